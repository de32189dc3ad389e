pub mod exit;
pub mod weather;
