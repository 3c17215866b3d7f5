pub mod fetch;
pub mod normalize;

pub use fetch::fetch;
pub use normalize::normalize;
