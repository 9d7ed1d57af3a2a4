pub mod multi_line;
pub mod theme;

pub use multi_line::returns_chart;
