pub mod calculator;
pub mod input_validator;

pub use calculator::CalculatorService;
pub use input_validator::InputValidator;
