//! Demo that runs a full icebreak-dimension detection over a sample call
//! transcript, rules only (vector search and LLM validation disabled).

use call_audit_engine::{engine_with_validator, offline_engine, DetectionConfig};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    // With an API key the real validator joins in; otherwise rules only.
    let engine = if std::env::var("OPENAI_API_KEY").is_ok() {
        engine_with_validator(DetectionConfig::default())
    } else {
        offline_engine(DetectionConfig::default())
    };
    let cfg = engine.config();
    println!(
        "threshold {:.2}, evidence cap {} chars",
        cfg.confidence_threshold, cfg.max_evidence_length
    );
    engine.probe_generator().await;

    let transcript = "您好，耽误您两分钟时间。我是益盟操盘手的服务专员，工号8021。\
        我们公司是上市公司，和券商有多年合作。今天免费给您讲解一下软件里\
        BS点的用法，B点买入信号，S点卖出信号，绝不会让您错过主升浪。";

    for category in ["icebreak", "deduction"] {
        let report = engine.detect_dimension(category, transcript).await;
        println!("== {category}: {}/{} hit ==", report.hits(), report.results.len());
        for pr in &report.results {
            println!(
                "  {:<28} hit={:<5} conf={:.2} via={} {}",
                pr.point,
                pr.result.hit,
                pr.result.confidence,
                pr.result.evidence_source.as_str(),
                pr.result.evidence,
            );
        }
        for w in &report.warnings {
            println!("  warning: {w}");
        }
    }

    println!("detect-demo done");
}
