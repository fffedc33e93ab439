pub mod hardsub;
pub mod ocr;
pub mod progress;
pub mod session;
pub mod settings;
pub mod subtitle;
pub mod timing;
