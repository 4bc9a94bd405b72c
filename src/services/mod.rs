pub mod autopick;
pub mod color_math;
pub mod generation;
pub mod hair_color;
pub mod identity;
pub mod imaging;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod style;
pub mod topup;
