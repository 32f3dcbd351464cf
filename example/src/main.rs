// example/src/main.rs

use serde_json::json;
use tagwire::{decode, encode, load_schema, verify, ConvertOptions, SchemaError};

// The message shapes a function host exchanges with its workers: a request
// written to the worker's stdin and a response read back from its stdout.
const SCHEMA: &str = r#"
    syntax = "proto3";
    package host;

    message HeaderFields {
      repeated string fields = 1;
    }

    message FDRequest {
      string method = 1;
      bytes body = 2;
      int64 content_length = 3;
      string host = 4;
      string remote_addr = 5;
      string request_uri = 6;
      map<string, HeaderFields> header = 7;
    }

    message FDResponse {
      bytes body = 1;
      int32 status_code = 2;
      int32 length = 3;
      map<string, HeaderFields> header = 4;
    }
"#;

fn main() -> Result<(), SchemaError> {
    let root = load_schema(SCHEMA)?;

    // Build a request the way the host would, as a plain object.
    let request = json!({
        "method": "POST",
        "body": [123, 125],
        "contentLength": 2,
        "host": "functions.internal",
        "remoteAddr": "10.0.0.9:41830",
        "requestUri": "/invoke/greeter",
        "header": {
            "Content-Type": { "fields": ["application/json"] },
            "X-Request-Id": { "fields": ["b2c9"] }
        }
    });

    if let Some(problem) = verify(&root, "host.FDRequest", &request) {
        return Err(SchemaError::Descriptor(problem));
    }

    let message = root.from_object("host.FDRequest", &request)?;
    let bytes = encode(&root, &message)?;
    println!("encoded request: {} bytes", bytes.len());

    // The worker decodes the request and answers.
    let received = decode(&root, "host.FDRequest", &bytes)?;
    let received_obj = root.to_object(&received, &ConvertOptions::default())?;
    println!(
        "worker sees method={} uri={}",
        received_obj["method"], received_obj["requestUri"]
    );

    let response = json!({
        "body": [111, 107],
        "statusCode": 200,
        "length": 2,
        "header": { "Content-Type": { "fields": ["text/plain"] } }
    });
    let response_msg = root.from_object("host.FDResponse", &response)?;
    let response_bytes = encode(&root, &response_msg)?;

    // Back on the host side.
    let answered = decode(&root, "host.FDResponse", &response_bytes)?;
    let answered_obj = root.to_object(&answered, &ConvertOptions::default())?;
    println!(
        "host sees status={} length={}",
        answered_obj["statusCode"], answered_obj["length"]
    );

    Ok(())
}
