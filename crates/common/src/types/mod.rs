mod ai_inference_log;
mod change_event;
mod discovered_api;
mod import_run;
mod offer;
mod page_type;
mod product;
mod source_page;

pub use ai_inference_log::*;
pub use change_event::*;
pub use discovered_api::*;
pub use import_run::*;
pub use offer::*;
pub use page_type::*;
pub use product::*;
pub use source_page::*;
