pub mod capture;
pub mod export;
