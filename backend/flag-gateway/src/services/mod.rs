pub mod coalescer;
pub mod country;
pub mod gateway;
pub mod origin;
pub mod signer;

pub use coalescer::Coalescer;
pub use country::{CountryLookup, StaticCountryLookup};
pub use gateway::{CacheStatus, FlagGateway, ResolvedFlag};
pub use origin::{HttpOriginProbe, OriginError, OriginFetcher, OriginProbe};
pub use signer::{SignatureGenerator, SignerError};
