// Header sniffing for the containers the host engine accepts.

pub mod format;
