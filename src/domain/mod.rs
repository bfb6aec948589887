pub mod clock;
pub mod donation;
pub mod events;
pub mod meal_unit;
pub mod metric;
pub mod reference;
pub mod time_slot;
pub mod voucher;

pub use clock::*;
pub use donation::*;
pub use events::*;
pub use meal_unit::*;
pub use metric::*;
pub use reference::*;
pub use time_slot::*;
pub use voucher::*;
