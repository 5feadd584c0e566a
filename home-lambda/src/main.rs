//! Runs the home handler on AWS Lambda behind the API Gateway proxy integration.
use emulator_types::{InvocationContext, InvocationEvent};
use lambda_runtime::{service_fn, Error, LambdaEvent};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // CloudWatch adds the ingestion time and does not render colors
    tracing_subscriber::fmt()
        .without_time()
        .with_ansi(false)
        .with_target(false)
        .init();

    let func = service_fn(|event: LambdaEvent<InvocationEvent>| async move {
        let (event, ctx) = event.into_parts();
        home_lambda::get_home(event, InvocationContext::from(ctx)).await
    });
    lambda_runtime::run(func).await?;

    Ok(())
}
