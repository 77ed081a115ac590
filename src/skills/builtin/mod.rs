pub mod code;

pub use code::CodeSkill;
