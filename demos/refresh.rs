use jwt_http::{ClientOptions, JwtHttpClient, TokenPair};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = ClientOptions::from_env().map_err(anyhow::Error::msg)?;
    let client = JwtHttpClient::builder()
        .options(options)
        .before(|| {
            println!("-> request");
            Ok(())
        })
        .after(|payload| {
            println!("<- {payload}");
            Ok(())
        })
        .build()?;

    let access = std::env::var("JWT_HTTP_ACCESS_TOKEN")?;
    let refresh = std::env::var("JWT_HTTP_REFRESH_TOKEN").ok();
    client.store_tokens(&TokenPair::new(access, refresh)).await?;

    let me = client.get("/me", ()).await?;
    println!("{me:#}");

    let order = client.post("/orders", json!({ "id": 12 })).await?;
    println!("{order:#}");

    Ok(())
}
