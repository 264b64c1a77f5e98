use sv_http::setup::Application;
use sv_http::{get_quit_notifier, telemetry};
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // We don't care if it can't find a .env file
    let _ = dotenv::dotenv();

    color_eyre::install()?;

    let subscriber = telemetry::create_subscriber(
        "WARN,reqwest=DEBUG,sv_system=DEBUG,sv_http=DEBUG,hyper=WARN",
    );
    subscriber.init();

    let config = sv_http::config::initialise_config()?;
    let app = Application::new(config).await?;

    let notifier = get_quit_notifier();

    app.run(notifier).await?;

    Ok(())
}
