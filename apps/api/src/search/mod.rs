// Opportunity search: research → analyze → aggregate → finalize.
// Upstream model calls go through the collaborator traits; everything else
// in this module is a pure transformation over `RunState`.

pub mod collaborators;
pub mod extractor;
pub mod handlers;
pub mod normalizer;
pub mod pipeline;
pub mod ranker;
pub mod report;
pub mod run_state;
