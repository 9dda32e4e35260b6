//! Gestione dei canali `session`: una task per canale che consuma le
//! richieste in ordine di arrivo.

pub mod dispatcher;
pub mod output;
pub mod request;

pub use dispatcher::{ChannelState, Dispatcher};
pub use output::{ChannelGone, ChannelOutput, SessionOutput};
pub use request::{ChannelEvent, ChannelRequest};
