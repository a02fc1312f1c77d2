pub mod environment;
pub mod paths;
pub mod settings;
pub mod sources;
pub mod validation;

pub use environment::*;
pub use paths::*;
pub use settings::*;
pub use sources::*;
pub use validation::*;
