pub mod api;
pub mod cloud;
pub mod db;
pub mod fiftyfive_api;
