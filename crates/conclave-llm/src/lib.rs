pub mod accumulate;
pub mod arguments;
pub mod cache;
pub mod factory;
pub mod reliable;

pub mod mock;

pub use accumulate::ToolCallAccumulator;
pub use arguments::{parse_tool_arguments, ParsedArguments};
pub use cache::BackendCache;
pub use factory::BackendFactory;
pub use mock::{MockBackend, MockResponse};
pub use reliable::{ReliableBackend, ReliableConfig};
