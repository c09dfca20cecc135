pub mod bash;
pub mod file_read;
pub mod file_write;

pub use bash::BashExecuteTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
