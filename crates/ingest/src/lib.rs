mod patch;
mod walker;

pub use patch::{diff_commit, looks_binary};
pub use walker::{CommitWalker, Git2RepoSource};
