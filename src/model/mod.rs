pub mod issue;
pub mod outcome;
