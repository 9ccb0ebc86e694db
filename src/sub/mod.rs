mod fetcher;

pub use fetcher::{parse_payload, RawNode, SubscriptionFetcher};
