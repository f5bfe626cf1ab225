use std::str::FromStr;
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

/// Client cli for payers and guests splitting a bill
#[derive(Parser, Debug)]
#[command(name = "tabsplit")]
#[command(about = "client cli used by payers and guests to split a bill", version, long_about = None
)]
struct Cli {
    #[arg(long, global = true, default_value = "http://localhost:8080", help = "Server base url")]
    host: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// payer side: bills and their items
    #[command(arg_required_else_help = true)]
    Bill(BillArgs),
    /// guest side: claims on a bill
    #[command(arg_required_else_help = true)]
    Claim(ClaimArgs),
    /// print a bill's live events until interrupted
    #[command(arg_required_else_help = true)]
    Watch { bill_id: Uuid },
}

#[derive(Debug, Args)]
struct BillArgs {
    #[command(subcommand)]
    command: BillCmds,
}

#[derive(Debug, Subcommand)]
enum BillCmds {
    #[command(arg_required_else_help = true)]
    Create(CreateArgs),
    #[command(arg_required_else_help = true)]
    Show { bill_id: Uuid },
    #[command(arg_required_else_help = true)]
    Share { token: String },
    #[command(arg_required_else_help = true)]
    Summary { bill_id: Uuid },
    #[command(arg_required_else_help = true)]
    Live { bill_id: Uuid },
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(long)]
    payer: String,
    #[arg(long, help = "Where guests send money")]
    handle: String,
    #[arg(long, help = "Reference of the uploaded receipt image")]
    image: String,
    #[arg(long)]
    restaurant: Option<String>,
    #[arg(long = "item", help = "Line item as NAME:QUANTITY:PRICE", value_name = "ITEM", num_args = 1.., required = true)]
    items: Vec<ItemSpec>,
}

#[derive(Debug, Clone, Serialize)]
struct ItemSpec {
    name: String,
    quantity: f64,
    price_per_unit: f64,
}

impl FromStr for ItemSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let (Some(price), Some(quantity), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("expected NAME:QUANTITY:PRICE, got {s}"));
        };
        Ok(Self {
            name: name.to_string(),
            quantity: quantity.parse().map_err(|e| format!("bad quantity {quantity}: {e}"))?,
            price_per_unit: price.parse().map_err(|e| format!("bad price {price}: {e}"))?,
        })
    }
}

#[derive(Debug, Args)]
struct ClaimArgs {
    #[command(subcommand)]
    command: ClaimCmds,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(short = 'b', long = "bill", help = "Bill id to operate")]
    bill_id: Uuid,
    #[arg(short = 's', long = "session", help = "Guest session id; a new one is generated when absent")]
    session_id: Option<Uuid>,
    #[arg(short = 'g', long = "guest")]
    guest_name: String,
}

#[derive(Debug, Subcommand)]
enum ClaimCmds {
    /// set the quantity of one item the guest takes
    #[command(arg_required_else_help = true)]
    Item {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(short = 'i', long = "item")]
        item_id: Uuid,
        #[arg(short = 'q', long)]
        quantity: f64,
    },
    #[command(arg_required_else_help = true)]
    Tip {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        amount: f64,
    },
    #[command(arg_required_else_help = true)]
    Submit {
        claim_id: Uuid,
        #[arg(long, help = "How the guest paid, e.g. VENMO")]
        method: Option<String>,
    },
    #[command(arg_required_else_help = true)]
    Confirm { claim_id: Uuid },
    #[command(arg_required_else_help = true)]
    Unconfirm { claim_id: Uuid },
    /// drop the session's in-progress claim
    #[command(arg_required_else_help = true)]
    Leave {
        #[arg(short = 'b', long = "bill")]
        bill_id: Uuid,
        #[arg(short = 's', long = "session")]
        session_id: Uuid,
    },
}

/// Send a request and print the JSON answer, or the server's error message.
async fn report(req: RequestBuilder) -> Result<(), anyhow::Error> {
    let res = req.send().await.context("request failed")?;
    let status = res.status();
    if status == StatusCode::NO_CONTENT {
        println!("done");
        return Ok(());
    }
    let body = res.json::<Value>().await.context("failed to get response, aborting")?;
    if status.is_success() {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
            bail!("{}: {}", status, body["message"].as_str().unwrap_or("no message"));
        }
        unexpected => bail!("got unexpected status code, {}", unexpected),
    }
}

fn session_id(session: &SessionArgs) -> Uuid {
    session.session_id.unwrap_or_else(|| {
        let id = Uuid::new_v4();
        println!("using new session={}", id);
        id
    })
}

async fn watch(client: &Client, host: &str, bill_id: Uuid) -> Result<(), anyhow::Error> {
    let res = client
        .get(format!("{}/v1/bills/{}/events", host, bill_id))
        .send()
        .await?
        .error_for_status()?;
    println!("watching bill={}, ctrl-c to stop", bill_id);
    let mut chunks = res.bytes_stream();
    let pump = async {
        while let Some(chunk) = chunks.next().await {
            print!("{}", String::from_utf8_lossy(&chunk?));
        }
        Ok::<_, anyhow::Error>(())
    };
    tokio::select! {
        ended = pump => {
            ended?;
            println!("server closed the stream");
        }
        _ = tokio::signal::ctrl_c() => println!("stopped"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let Cli { host, command } = Cli::parse();
    let client = Client::new();

    match command {
        Commands::Bill(bill) => match bill.command {
            BillCmds::Create(args) => {
                report(client.post(format!("{}/v1/bills", host)).json(&json!({
                    "payer_name": args.payer,
                    "payment_handle": args.handle,
                    "image_ref": args.image,
                    "restaurant_name": args.restaurant,
                    "items": args.items,
                })))
                .await?
            }
            BillCmds::Show { bill_id } => report(client.get(format!("{}/v1/bills/{}", host, bill_id))).await?,
            BillCmds::Share { token } => report(client.get(format!("{}/v1/share/{}", host, token))).await?,
            BillCmds::Summary { bill_id } => report(client.get(format!("{}/v1/bills/{}/summary", host, bill_id))).await?,
            BillCmds::Live { bill_id } => report(client.get(format!("{}/v1/bills/{}/live", host, bill_id))).await?,
        },
        Commands::Claim(claim) => match claim.command {
            ClaimCmds::Item { session, item_id, quantity } => {
                report(client.post(format!("{}/v1/claims/items", host)).json(&json!({
                    "bill_id": session.bill_id,
                    "item_id": item_id,
                    "session_id": session_id(&session),
                    "guest_name": session.guest_name,
                    "quantity": quantity,
                })))
                .await?
            }
            ClaimCmds::Tip { session, amount } => {
                report(client.post(format!("{}/v1/claims/tip", host)).json(&json!({
                    "bill_id": session.bill_id,
                    "session_id": session_id(&session),
                    "guest_name": session.guest_name,
                    "tip_amount": amount,
                })))
                .await?
            }
            ClaimCmds::Submit { claim_id, method } => {
                report(
                    client
                        .post(format!("{}/v1/claims/{}/submit", host, claim_id))
                        .json(&json!({ "settlement_method": method })),
                )
                .await?
            }
            ClaimCmds::Confirm { claim_id } => {
                report(client.post(format!("{}/v1/claims/{}/confirm", host, claim_id))).await?
            }
            ClaimCmds::Unconfirm { claim_id } => {
                report(client.post(format!("{}/v1/claims/{}/unconfirm", host, claim_id))).await?
            }
            ClaimCmds::Leave { bill_id, session_id } => {
                report(client.delete(format!("{}/v1/bills/{}/sessions/{}", host, bill_id, session_id))).await?
            }
        },
        Commands::Watch { bill_id } => watch(&client, &host, bill_id).await?,
    };
    Ok(())
}
