//! Dumps the OpenAPI document for the Mentor API as JSON to stdout.

use mentor_api::router::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    println!("{}", ApiDoc::openapi().to_pretty_json()?);
    Ok(())
}
