pub mod basis;
pub mod helper;
pub mod symmetry;
pub mod tensor;

mod basis_test;
