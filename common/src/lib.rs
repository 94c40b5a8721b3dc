mod codec;
mod constants;
mod game_state;
mod protocol;
mod replay;
mod tagged;

pub mod point;

pub use codec::*;
pub use constants::*;
pub use game_state::*;
pub use protocol::*;
pub use replay::*;
pub use tagged::*;
