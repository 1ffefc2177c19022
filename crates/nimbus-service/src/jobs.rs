//! Builtin job functions, registered at startup.
//!
//! Jobs write their output through the execution context; it lands in the
//! `logs` column of the job's history rows.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use nimbus_scheduler::{JobError, JobRegistry};

/// Register the builtin job functions under their `jobs:` references.
pub fn register_builtin_jobs(registry: &Arc<JobRegistry>) {
    registry.register_async("jobs:cleanup_old_data", |ctx, _args, _kwargs| async move {
        ctx.log("Starting cleanup_old_data job");
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.log("Cleanup completed successfully");
        Ok(())
    });

    registry.register_async(
        "jobs:send_notification_email",
        |ctx, args, _kwargs| async move {
            let user_id = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| JobError::new("user id argument required"))?
                .to_string();
            let message = args
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ctx.log(format!(
                "Starting send_notification_email job for user {user_id}"
            ));
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.log(format!("Email sent to user {user_id}: {message}"));
            Ok(())
        },
    );

    registry.register_async(
        "jobs:process_large_dataset",
        |ctx, args, kwargs| async move {
            let dataset_id = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| JobError::new("dataset id argument required"))?
                .to_string();
            let batch_size = kwargs
                .get("batch_size")
                .and_then(Value::as_u64)
                .unwrap_or(1000);
            ctx.log(format!(
                "Starting process_large_dataset job for dataset {dataset_id} with batch_size {batch_size}"
            ));
            let total_batches = 10;
            for batch in 1..=total_batches {
                ctx.log(format!(
                    "Processing batch {batch}/{total_batches} for dataset {dataset_id}"
                ));
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            ctx.log(format!(
                "Dataset {dataset_id} processing completed successfully"
            ));
            Ok(())
        },
    );

    registry.register_async("jobs:generate_report", |ctx, args, _kwargs| async move {
        let report_type = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
            .to_string();
        ctx.log(format!("Starting generate_report job: {report_type}"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.log(format!("Report {report_type} generated successfully"));
        Ok(())
    });

    registry.register_async("jobs:health_check", |ctx, _args, _kwargs| async move {
        ctx.log("Running health check");
        ctx.log("Health check passed");
        Ok(())
    });

    tracing::info!(functions = registry.names().len(), "Builtin jobs registered");
}
