use crate::config::{Settings, SinkSettings};
use crate::proxy::service::{build_router, ProxyService};
use crate::proxy::sink::{JsonLinesSink, RecordSink, TracingSink};
use crate::site::Site;
use crate::{Error, Result};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    router: Router,
}

impl Application {
    #[instrument]
    pub fn new() -> Result<Self> {
        let settings = Settings::new()?;

        let sink = build_sink(&settings.sink)?;
        let proxy_config = settings
            .proxy
            .to_proxy_config()
            .map_err(Error::InvalidSettings)?;

        info!(
            route_prefix = %proxy_config.route_prefix,
            upstream = %proxy_config.upstream_url,
            "Configuring proxy"
        );

        let proxy = ProxyService::new(proxy_config, Arc::clone(&sink))?;
        let site = Arc::new(Site::new(
            PathBuf::from(&settings.site.root),
            settings.site.blocked_routes.clone(),
        ));
        let router = build_router(proxy, site, sink);

        Ok(Self { settings, router })
    }

    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let address = format!(
            "{}:{}",
            self.settings.application.host, self.settings.application.port
        );
        info!("Starting glasswire server on {address}");

        let listener = tokio::net::TcpListener::bind(&address).await?;
        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Build the record sink from settings; the same handle is threaded through
/// every emitting component.
fn build_sink(settings: &SinkSettings) -> Result<Arc<dyn RecordSink>> {
    match settings.output.as_str() {
        "stdout" => Ok(Arc::new(JsonLinesSink::stdout())),
        "tracing" => Ok(Arc::new(TracingSink)),
        "file" => {
            let path = settings.path.as_deref().ok_or_else(|| {
                Error::InvalidSettings("sink.path is required when sink.output is 'file'".into())
            })?;
            Ok(Arc::new(JsonLinesSink::file(path)?))
        }
        other => Err(Error::InvalidSettings(format!(
            "unknown sink.output '{other}' (expected stdout, tracing, or file)"
        ))),
    }
}
