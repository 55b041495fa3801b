pub mod external;
pub mod presence;
