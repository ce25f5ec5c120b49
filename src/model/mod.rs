pub mod capture;
pub mod device;
pub mod payload;
pub mod user;
