pub mod returns;

pub use returns::ReturnsTable;
