pub mod claim;
pub mod rate;
pub mod shop;

pub use claim::{ClaimToken, NewClaimToken};
pub use rate::{CurrencyPair, Rate, RateQuote};
pub use shop::{NewShop, Shop, ShopUpdate};
