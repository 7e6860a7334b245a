// Adapters: concrete collaborators for the core transform (HTTP, page formats, sinks)

pub mod http;
pub mod page;
pub mod sink;
