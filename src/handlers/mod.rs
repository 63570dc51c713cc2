mod calc;
mod health;
mod history;

pub use calc::{add, divide, multiply, subtract};
pub use health::{healthz, home, method_not_allowed, not_found};
pub use history::history;
