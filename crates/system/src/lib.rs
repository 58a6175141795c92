pub mod dispatcher;
pub mod operator;
pub mod utils;

pub use dispatcher::*;
pub use operator::*;
pub use utils::*;
