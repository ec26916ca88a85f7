pub mod apply;
pub mod disambiguate;
pub mod health;
pub mod jobs;
pub mod plan;
pub mod scan;
