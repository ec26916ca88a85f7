use serde::de::DeserializeOwned;

use super::ProviderError;

/// Decode a JSON body after mapping HTTP failures onto the provider error
/// taxonomy. 429 carries any `Retry-After` seconds along.
pub(super) async fn json_or_error<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::Parse(err.to_string()));
    }

    match status.as_u16() {
        404 => Err(ProviderError::NotFound),
        401 | 403 => Err(ProviderError::Auth(format!("status {status}"))),
        code => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| raw.trim().parse::<u64>().ok());
            Err(ProviderError::Status { code, retry_after })
        }
    }
}

/// Parse a year out of provider date strings like `2015-09-28` or `2015`.
pub(super) fn year_from_date(raw: &str) -> Option<i32> {
    let prefix: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    if prefix.len() == 4 {
        prefix.parse().ok()
    } else {
        None
    }
}
