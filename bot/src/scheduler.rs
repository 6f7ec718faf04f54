use anyhow::Result;
use log::error;
use std::future::Future;
use std::time::Duration;
use steam::Exchange;
use tokio_cron_scheduler::{Job, JobScheduler};

pub(crate) struct Scheduler {
    exchange: Exchange,
    scheduler: JobScheduler,
}

impl Scheduler {
    pub(crate) async fn new(exchange: Exchange) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Scheduler {
            exchange,
            scheduler,
        })
    }

    pub(crate) async fn schedule_task<F, Fut>(&self, every: Duration, task: F) -> Result<()>
    where
        F: Fn(Exchange) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let exchange = self.exchange.clone();

        self.scheduler
            .add(Job::new_repeated_async(every, move |_uuid, _l| {
                let fut = task(exchange.clone());
                Box::pin(async move {
                    if let Err(e) = fut.await {
                        error!("Error executing scheduled task: {e:?}");
                    }
                })
            })?)
            .await?;

        Ok(())
    }

    pub(crate) async fn schedule_tasks(&self) -> Result<()> {
        let config = self.exchange.config();

        self.schedule_task(config.sell_interval(), |exchange| async move {
            sell_pass(&exchange).await
        })
        .await?;

        self.schedule_task(config.sell_interval(), |exchange| async move {
            exchange.sync_market_events().await?;
            Ok(())
        })
        .await?;

        if let Some(every) = config.heartbeat() {
            self.schedule_task(every, |_| async move {
                log::info!("Bot heartbeat.");
                Ok(())
            })
            .await?;
        }

        Ok(())
    }

    pub(crate) async fn start(&self) -> Result<()> {
        self.schedule_tasks().await?;
        self.scheduler.start().await?;
        Ok(())
    }

    pub(crate) async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

pub(crate) async fn sell_pass(exchange: &Exchange) -> Result<()> {
    let reports = exchange.sell_loop().await?;
    let listed: usize = reports.iter().map(|r| r.listed).sum();
    let delisted: usize = reports.iter().map(|r| r.delisted).sum();
    log::info!(
        "Sell pass done: {} items, {listed} listed, {delisted} delisted",
        reports.len()
    );
    Ok(())
}
