pub mod aggregate;
pub mod cursor;
pub mod exec_expr;
pub mod exec_query;
pub mod scope;
pub mod window;
