//! Site command handler.

use tabled::Tabled;

use kumo_api::models::Site;
use kumo_core::CoreError;

use crate::cli::GlobalOpts;
use crate::config::Session;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct SiteRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
}

fn site_row(site: &Site) -> SiteRow {
    SiteRow {
        id: site.id.clone(),
        name: site.display_name().to_owned(),
    }
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let session = Session::open(global)?;
    let sites = session
        .client
        .list_sites()
        .await
        .map_err(|e| session.auth_context(CoreError::from(e).into()))?;

    let out = output::render_list(global.output, &sites, site_row, |s| s.id.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}
