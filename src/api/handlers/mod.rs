pub mod banners;
pub mod health;
pub mod uploads;
