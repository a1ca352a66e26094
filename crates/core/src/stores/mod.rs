pub mod pinecone;

pub use pinecone::{PineconeControl, PineconeIndex};
