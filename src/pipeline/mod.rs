//! 索引与查询两条流水线
//!
//! 所有外部服务都以 trait 对象的形式注入，在进程启动时构造一次，之后只读共享

mod fetch;
mod ingest;
mod query;

pub use self::fetch::*;
pub use self::ingest::*;
pub use self::query::*;
