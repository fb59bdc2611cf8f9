pub mod citation;
pub mod conceptual;
pub mod semantic;
pub mod structural;
pub mod temporal;
