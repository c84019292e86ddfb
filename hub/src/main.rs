mod acquisition;
mod actuation;
mod app;
mod clock;
mod engine;
mod health;
mod host;
mod http;
mod mqtt;
mod publication;
mod queues;
mod sim;
mod store;
mod w1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
