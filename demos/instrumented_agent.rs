//! Instrumented agent demonstration
//!
//! This example wraps a small rule-based "weather agent" with evaluation
//! instrumentation. It demonstrates:
//! - Describing an agent as an `AgentTarget` with sync, async and streaming methods
//! - Streaming plain text chunks while single-shot methods return a full reply
//! - Recording nested tool calls with `tool_trace`
//! - Collecting evaluation dataset rows through a durable store
//! - Inspecting everything that was shipped with `RecordingSink`
//!
//! # Running the example
//!
//! ```bash
//! RUST_LOG=debug cargo run --example instrumented_agent
//! ```

use agent_evaluation::prelude::*;
use agent_evaluation::telemetry::{RecordCallback, TelemetryEvent};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
struct Reply {
    text: String,
    model: String,
    usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug)]
struct WeatherError(String);

impl fmt::Display for WeatherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn lookup_forecast(city: &str) -> std::result::Result<&'static str, WeatherError> {
    match city.to_lowercase().as_str() {
        "toronto" => Ok("light snow"),
        "lisbon" => Ok("sunny"),
        other => Err(WeatherError(format!("no station near {}", other))),
    }
}

fn reply(prompt: &str, text: String) -> Reply {
    Reply {
        usage: Usage {
            input_tokens: prompt.split_whitespace().count() as u64,
            output_tokens: text.split_whitespace().count() as u64,
        },
        text,
        model: "rule-based-v1".to_string(),
    }
}

fn weather_agent() -> AgentTarget<String, Reply, WeatherError, String> {
    let forecast = tool_trace("forecast");

    AgentTarget::new("weather-agent")
        .with_method(
            "generate_content",
            AgentMethod::sync(move |prompt: String, ctx: CallContext| {
                let city = prompt.split_whitespace().last().unwrap_or_default().to_string();
                let weather = forecast.call(&ctx, || lookup_forecast(&city))?;
                Ok(reply(&prompt, format!("Expect {} in {}.", weather, city)))
            }),
        )
        .with_method(
            "run_async",
            AgentMethod::future(|prompt: String, ctx: CallContext| async move {
                let greeting = tool_trace("greeting")
                    .call_async(&ctx, async { Ok::<_, WeatherError>("Hello from the weather desk") })
                    .await?;
                Ok(reply(&prompt, greeting.to_string()))
            }),
        )
        .with_method(
            "generate_content_stream",
            AgentMethod::stream(|prompt: String, _ctx: CallContext| {
                let words: Vec<std::result::Result<String, WeatherError>> =
                    ["Clear", "skies", "ahead."]
                        .iter()
                        .map(|word| Ok(format!("{} ", word)))
                        .collect();
                tracing::debug!(prompt = %prompt, chunks = words.len(), "Streaming outlook");
                stream::iter(words)
            }),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = EvaluationConfig::from_env("demo-project", "weather-agent")?;
    config.dataset.auto_collect = true;
    config.dataset.buffer_size = 2;

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("{}", e);
    }

    println!("{}", "=".repeat(80));
    println!("Instrumented Agent Demonstration");
    println!("{}", "=".repeat(80));

    let on_record: RecordCallback = Arc::new(|event: &TelemetryEvent| {
        println!("  -> {}", event.record().printable_summary().lines().next().unwrap_or(""));
    });
    let recording = Arc::new(RecordingSink::new(Some(on_record)));

    let wrapper = EvaluationWrapper::builder(weather_agent(), config)
        .sinks(Sinks::all(recording.clone()))
        .error_type(|e: &WeatherError| {
            if e.0.starts_with("no station") {
                "NoStation".to_string()
            } else {
                "WeatherError".to_string()
            }
        })
        .build()?;

    println!("\nPrimary entry point: {}", wrapper.primary_method());
    println!("Instrumented: {:?}\n", wrapper.instrumented_methods());

    let generate = wrapper.sync_method("generate_content")?;
    for prompt in ["Weather in Toronto", "Weather in Lisbon", "Weather in Atlantis"] {
        match generate.call(prompt.to_string()) {
            Ok(answer) => println!("{} => {}", prompt, answer.text),
            Err(e) => println!("{} => error: {}", prompt, e),
        }
    }

    let greeting = wrapper.async_method("run_async")?.call("Hi".to_string()).await;
    if let Ok(answer) = greeting {
        println!("Hi => {}", answer.text);
    }

    let mut words = wrapper.stream_method("generate_content_stream")?.call("Outlook?".to_string());
    print!("Outlook? =>");
    while let Some(Ok(chunk)) = words.next().await {
        print!(" {}", chunk.trim_end());
    }
    println!();

    wrapper.record_custom_metric("demo_quality", 0.9);

    println!("\nShipping telemetry...");
    wrapper.shutdown().await;

    println!("\n{}", "=".repeat(80));
    println!("Summary");
    println!("{}", "=".repeat(80));
    println!("Interactions logged: {}", recording.interactions().len());
    println!("Errors logged:       {}", recording.errors().len());
    println!("Tool calls:          {}", recording.tool_calls().len());
    println!("Spans:               {}", recording.spans().len());
    println!("Metric samples:      {}", recording.metrics().len());
    println!("Dataset rows:        {}", recording.dataset_rows().len());

    println!("\nLast 3 records:");
    for summary in recording.get_last_n_summaries(3, None) {
        println!("{}\n", summary);
    }

    Ok(())
}
