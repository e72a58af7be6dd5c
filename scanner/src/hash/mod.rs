pub mod bank;
pub mod phash;
pub mod traits;

pub use bank::TemplateBank;
pub use phash::PerceptualHasher;
pub use traits::FrameHasher;
