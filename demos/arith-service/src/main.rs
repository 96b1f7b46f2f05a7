use serde_json::json;

use girder_transport::init_tracing;

#[tokio::main]
async fn main() -> girder_transport::Result<()> {
    init_tracing();

    let server = arith_service::builder().build()?;
    server.with_metrics();
    server.with_log();

    let addr = server.serve("0.0.0.0:8080".parse().expect("static addr")).await?;
    tracing::info!(%addr, "arith-service up");

    server
        .serve_health(
            "/healthz",
            "0.0.0.0:8081".parse().expect("static addr"),
            &json!({"status": "ok"}),
        )
        .await?;
    server
        .serve_metrics("/metrics", "0.0.0.0:8082".parse().expect("static addr"))
        .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown().await
}
