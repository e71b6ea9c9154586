mod oracle;
pub use oracle::*;

mod counting;
pub use counting::*;

mod parallel;
pub use parallel::*;

mod subprocess;
pub use subprocess::*;

mod adaptive;
pub use adaptive::*;

mod experiment;
pub use experiment::*;
