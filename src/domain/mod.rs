mod ledger;
mod money;
mod product;
mod transaction;
mod wallet;

pub use ledger::*;
pub use money::*;
pub use product::*;
pub use transaction::*;
pub use wallet::*;
