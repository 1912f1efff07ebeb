pub mod page;
pub mod price;
pub mod timestamp;
