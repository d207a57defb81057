use std::sync::Arc;

use bson::doc;
use combee::{Category, FieldValue, MemoryJobStore, NewJob, Predicate, QueryEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Swap in `MongoDbJobStore` to look at a real aide-de-camp database.
    let engine = QueryEngine::new("mail", Arc::new(MemoryJobStore::new())).with_batch_size(10);

    for n in 0..35 {
        let status = if n % 7 == 0 { "stuck" } else { "ok" };
        engine
            .create_job(NewJob::new("send_email", doc! { "n": n, "status": status }))
            .await?;
    }

    let stuck = engine
        .find(Category::Waiting, doc! { "data.status": "stuck" })
        .await?;
    println!("stuck: {:?}", stuck.iter().map(|job| &job.data).collect::<Vec<_>>());

    let high = Predicate::new(|job: &combee::JobRecord| {
        matches!(job.field("data.n"), FieldValue::Present(bson::Bson::Int32(n)) if n >= 30)
    });
    println!("n >= 30: {}", engine.count(Category::Waiting, high).await?);

    let statuses = engine
        .distinct(Category::Waiting, "data.status", doc! {})
        .await?;
    for (value, count) in statuses.iter() {
        println!("{value}: {count}");
    }

    let report = engine
        .remove_matching(Category::Waiting, doc! { "data.status": "stuck" })
        .await?;
    println!("removed {} jobs", report.removed);
    Ok(())
}
