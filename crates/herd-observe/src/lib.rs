mod logger;
pub use logger::*;

mod span;
pub use span::job_span;
