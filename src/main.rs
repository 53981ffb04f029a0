use anyhow::Result;
use tracing::info;

use dynamo_model::config::AppConfig;
use dynamo_model::dynamodb::{
    AttributeConfig, AwsDynamoDb, Item, Model, ModelConfig, ModelOptions, QueryInput, Schema,
    TableSetup, UpdateOptions, Value, WhereQuery,
};
use dynamo_model::logging;

const PARTITION_KEY: &str = "category";
const SORT_KEY: &str = "product_name";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = AppConfig::from_env()?;
    logging::init_logging(config.log_level)?;

    let sdk_config = aws_config::load_from_env().await;
    let client = AwsDynamoDb::new(&sdk_config);
    client.check_auth().await?;

    let table_keys = Schema::new()
        .attribute(PARTITION_KEY, AttributeConfig::string().required().hash_key())
        .attribute(SORT_KEY, AttributeConfig::string().required().range_key());
    let schema = Schema::new()
        .attribute("price", AttributeConfig::number().required())
        .attribute(
            "tags",
            AttributeConfig::array(AttributeConfig::string())
                .default_value(Value::List(Vec::new())),
        );

    let products = Model::new(
        client,
        ModelConfig::new("Product", &config.table_name, table_keys, schema).options(ModelOptions {
            timestamps: true,
            ..ModelOptions::default()
        }),
    )?;

    products
        .ensure_table(&TableSetup {
            create_if_missing: config.create_table,
            ..TableSetup::default()
        })
        .await?;

    let item = products
        .upsert(
            Item::new()
                .set(PARTITION_KEY, "tools")
                .set(SORT_KEY, "hammer")
                .set("price", 12.5),
        )
        .await?;
    info!("Upserted: {:?}", item);

    let keys = Item::new().set(PARTITION_KEY, "tools").set(SORT_KEY, "hammer");
    let updated = products
        .update(keys.clone(), Item::new().set("price", 14.0), UpdateOptions::default())
        .await?;
    info!("Updated: {:?}", updated);

    let tools = products
        .query(QueryInput::where_clause(
            WhereQuery::new().value(PARTITION_KEY, "tools"),
        ))
        .await?;
    info!("Found {} item(s) in category 'tools'", tools.len());

    if let Some(deleted) = products.delete(keys).await? {
        info!("Deleted: {:?}", deleted);
    }

    Ok(())
}
