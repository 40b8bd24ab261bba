pub mod manifest;
pub mod merge_service;
pub mod merger;
pub mod purge;
pub mod reducer;
pub mod session;
pub mod splitter;
pub mod stager;
pub mod storage;
