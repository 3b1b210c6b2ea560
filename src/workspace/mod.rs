//! 工作区：文件 I/O 边界与项目快照

pub mod disk;
pub mod io;
pub mod snapshot;

pub use disk::DiskFileIo;
pub use io::{FileIo, FileMapSupplier, IoRecord, MemoryFileIo};
pub use snapshot::{DirectorySnapshot, DEFAULT_IGNORE};
