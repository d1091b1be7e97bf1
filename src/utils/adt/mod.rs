pub mod datetime;
pub mod json;
pub mod math_functions;
pub mod misc;
pub mod string_functions;
