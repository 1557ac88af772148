pub mod app_data;
pub mod bubble;
pub mod page_router;

pub use app_data::ChatViewData;
pub use bubble::{format_time, BubbleKind, BubbleView, Names};
pub use page_router::{Page, PageRouter};
