//! Web-search collaborator for `web_search` actions.

use anyhow::Result;

pub trait WebSearch {
    /// Answer `query` with a short textual summary.
    fn search(&mut self, query: &str) -> Result<String>;
}
