use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use model_serving::{JsonApi, Registry};
use serde_json::{Value, json};

fn scratch_repo() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("model-serving-{}-{nanos}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Three well separated clusters, one per class.
fn write_clusters(repo: &PathBuf) {
    let mut text = String::from("Id,x,y,Class\n");
    for i in 0..90 {
        let class = i % 3;
        let jitter = (i / 3) as f32 * 0.01;
        let (x, y) = match class {
            0 => (0.1 + jitter, 0.1),
            1 => (0.9 - jitter, 0.1),
            _ => (0.5, 0.9 - jitter),
        };
        text.push_str(&format!("{i},{x},{y},{}\n", class + 1));
    }
    fs::write(repo.join("train.csv"), text).unwrap();
}

fn parse(out: String) -> Value {
    serde_json::from_str(&out).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn async_training_over_a_csv_repository() {
    let repo = scratch_repo();
    write_clusters(&repo);

    let api = JsonApi::new(Arc::new(Registry::new(16)));
    let create = json!({
        "mllib": "softmax",
        "description": "forest classifier",
        "type": "supervised",
        "model": {"repository": repo},
        "parameters": {"input": {"connector": "csv"}, "mllib": {"nclasses": 3}}
    });
    let out = api.service_create("svc", &create.to_string()).await;
    assert_eq!(out, r#"{"status":{"code":201,"msg":"Created"}}"#);

    let train = json!({
        "service": "svc",
        "async": true,
        "parameters": {
            "input": {"label": "Class", "id": "Id", "label_offset": -1, "shuffle": true, "test_split": 0.1},
            "mllib": {"solver": {"iterations": 250, "base_lr": 0.5}, "net": {"batch_size": 16}, "seed": 5},
            "output": {"measure": ["acc", "mcll", "f1"], "measure_hist": true}
        }
    });
    let v = parse(api.service_train(&train.to_string()).await);
    assert_eq!(v["status"]["code"], 201);
    assert_eq!(v["head"]["job"], 1);
    assert_eq!(v["head"]["status"], "running");

    let status = json!({"service": "svc", "job": 1, "timeout": 1}).to_string();
    let v = loop {
        let v = parse(api.service_train_status(&status).await);
        assert_eq!(v["status"]["code"], 200, "{v}");
        if v["head"]["status"] != "running" {
            break v;
        }
    };

    assert_eq!(v["head"]["status"], "finished");
    assert!(v["body"]["measure"]["train_loss"].as_f64().unwrap() > 0.0);
    assert!(v["body"]["measure"]["iteration"].as_f64().unwrap() > 0.0);
    assert_eq!(v["body"]["measure"]["acc"], v["body"]["measure"]["accp"]);
    assert!(!v["body"]["measure_hist"]["train_loss_hist"].as_array().unwrap().is_empty());

    let predict = json!({
        "service": "svc",
        "parameters": {"output": {"best": 3}},
        "data": ["0.1,0.1", "0.5,0.9"]
    });
    let v = parse(api.service_predict(&predict.to_string()).await);
    assert_eq!(v["status"]["code"], 200, "{v}");
    let predictions = v["body"]["predictions"].as_array().unwrap();
    assert_eq!(predictions[0]["classes"][0]["cat"], "0");
    assert_eq!(predictions[1]["classes"][0]["cat"], "2");
    assert!(predictions[0]["classes"][0]["prob"].as_f64().unwrap() > 0.0);

    let out = api.service_delete("svc", r#"{"clear":"lib"}"#).await;
    assert_eq!(out, r#"{"status":{"code":200,"msg":"OK"}}"#);
    assert!(!repo.join("model_iter_250.json").exists());

    fs::remove_dir_all(&repo).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn image_service_needs_input_dimensions() {
    let repo = scratch_repo();
    let item = repo.join("sample.pgm");
    fs::write(&item, b"P2\n2 2\n255\n0 64\n128 255\n").unwrap();

    let api = JsonApi::new(Arc::new(Registry::new(16)));
    let create = json!({
        "mllib": "softmax",
        "model": {"repository": repo},
        "parameters": {"input": {"connector": "image"}}
    });
    let out = api.service_create("img", &create.to_string()).await;
    assert_eq!(out, r#"{"status":{"code":201,"msg":"Created"}}"#);

    let predict = json!({"service": "img", "parameters": {"input": {"bw": true}}, "data": [item]});
    let v = parse(api.service_predict(&predict.to_string()).await);
    assert_eq!(v["status"]["code"], 500);
    assert_eq!(v["status"]["dd_code"], 1007);

    fs::remove_dir_all(&repo).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_repository_is_a_bad_request() {
    let api = JsonApi::new(Arc::new(Registry::new(16)));
    let create = json!({
        "mllib": "softmax",
        "model": {"repository": "/definitely/not/here"},
        "parameters": {"input": {"connector": "csv"}}
    });

    let v = parse(api.service_create("svc", &create.to_string()).await);
    assert_eq!(v["status"]["code"], 400);
    assert_eq!(v["status"]["dd_code"], 1006);

    let create = json!({
        "mllib": "softmax",
        "model": {"repository": std::env::temp_dir()},
        "parameters": {"input": {"connector": "text"}}
    });
    let v = parse(api.service_create("svc", &create.to_string()).await);
    assert_eq!(v["status"]["dd_code"], 1004);
}
