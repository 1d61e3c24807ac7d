use std::io::{Cursor, Read};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use calamine::{Reader, Xlsx};
use geo::{HaversineBearing, HaversineDistance, Point};
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, Module};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};

use crate::script::script_err;

/// Registers the curated library modules under stable names.
pub fn register(engine: &mut Engine) {
    engine.register_static_module("json", json_module().into());
    engine.register_static_module("yaml", yaml_module().into());
    engine.register_static_module("csv", csv_module().into());
    engine.register_static_module("b64", base64_module().into());
    engine.register_static_module("re", regex_module().into());
    engine.register_static_module("hash", hash_module().into());
    engine.register_static_module("time", time_module().into());
    engine.register_static_module("math", math_module().into());
    engine.register_static_module("html", html_module().into());
    engine.register_static_module("xlsx", xlsx_module().into());
    engine.register_static_module("zip", zip_module().into());
    engine.register_static_module("geo", geo_module().into());
}

fn json_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("dumps", |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
        serde_json::to_string(&value).map_err(|e| script_err(format!("not JSON serialisable: {e}")))
    });
    module.set_native_fn("loads", |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| script_err(format!("invalid JSON: {e}")))?;
        to_dynamic(&value).map_err(|e| script_err(e.to_string()))
    });
    module
}

fn yaml_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("dumps", |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
        let value: serde_yaml::Value =
            from_dynamic(&value).map_err(|e| script_err(e.to_string()))?;
        serde_yaml::to_string(&value).map_err(|e| script_err(format!("not YAML serialisable: {e}")))
    });
    module.set_native_fn("loads", |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| script_err(format!("invalid YAML: {e}")))?;
        to_dynamic(&value).map_err(|e| script_err(e.to_string()))
    });
    module
}

fn csv_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("parse", |text: &str| -> Result<Array, Box<EvalAltResult>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let mut rows = Array::new();
        for record in reader.records() {
            let record = record.map_err(|e| script_err(format!("invalid CSV: {e}")))?;
            let row: Array = record
                .iter()
                .map(|field| Dynamic::from(field.to_string()))
                .collect();
            rows.push(Dynamic::from(row));
        }
        Ok(rows)
    });
    module
}

fn base64_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("encode", |text: &str| -> Result<String, Box<EvalAltResult>> {
        Ok(BASE64.encode(text.as_bytes()))
    });
    module.set_native_fn("encode", |bytes: Blob| -> Result<String, Box<EvalAltResult>> {
        Ok(BASE64.encode(&bytes))
    });
    module.set_native_fn("decode", |text: &str| -> Result<Blob, Box<EvalAltResult>> {
        BASE64
            .decode(text)
            .map_err(|e| script_err(format!("invalid base64: {e}")))
    });
    module
}

fn regex_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn(
        "matches",
        |pattern: &str, text: &str| -> Result<bool, Box<EvalAltResult>> {
            Ok(compile(pattern)?.is_match(text))
        },
    );
    module.set_native_fn(
        "find_all",
        |pattern: &str, text: &str| -> Result<Array, Box<EvalAltResult>> {
            let re = compile(pattern)?;
            Ok(re
                .find_iter(text)
                .map(|m| Dynamic::from(m.as_str().to_string()))
                .collect())
        },
    );
    module.set_native_fn(
        "replace_all",
        |pattern: &str, text: &str, replacement: &str| -> Result<String, Box<EvalAltResult>> {
            Ok(compile(pattern)?.replace_all(text, replacement).into_owned())
        },
    );
    module
}

fn compile(pattern: &str) -> Result<regex::Regex, Box<EvalAltResult>> {
    regex::Regex::new(pattern).map_err(|e| script_err(format!("invalid pattern: {e}")))
}

fn hash_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("sha256", |text: &str| -> Result<String, Box<EvalAltResult>> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    });
    module
}

fn time_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("now", || -> Result<String, Box<EvalAltResult>> {
        Ok(chrono::Utc::now().to_rfc3339())
    });
    module
}

fn math_module() -> Module {
    let mut module = Module::new();
    module.set_var("pi", std::f64::consts::PI);
    module.set_var("e", std::f64::consts::E);
    module.set_native_fn("abs", |x: f64| -> Result<f64, Box<EvalAltResult>> { Ok(x.abs()) });
    module.set_native_fn("abs", |x: i64| -> Result<i64, Box<EvalAltResult>> { Ok(x.abs()) });
    module.set_native_fn("sqrt", |x: f64| -> Result<f64, Box<EvalAltResult>> { Ok(x.sqrt()) });
    module.set_native_fn("sqrt", |x: i64| -> Result<f64, Box<EvalAltResult>> {
        Ok((x as f64).sqrt())
    });
    module.set_native_fn("pow", |x: f64, y: f64| -> Result<f64, Box<EvalAltResult>> {
        Ok(x.powf(y))
    });
    module.set_native_fn("pow", |x: i64, y: i64| -> Result<f64, Box<EvalAltResult>> {
        Ok((x as f64).powf(y as f64))
    });
    module.set_native_fn("floor", |x: f64| -> Result<f64, Box<EvalAltResult>> { Ok(x.floor()) });
    module.set_native_fn("ceil", |x: f64| -> Result<f64, Box<EvalAltResult>> { Ok(x.ceil()) });
    module.set_native_fn("round", |x: f64| -> Result<f64, Box<EvalAltResult>> { Ok(x.round()) });
    module.set_native_fn("log", |x: f64| -> Result<f64, Box<EvalAltResult>> { Ok(x.ln()) });
    module.set_native_fn("log", |x: f64, base: f64| -> Result<f64, Box<EvalAltResult>> {
        Ok(x.log(base))
    });
    module
}

fn html_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn(
        "select",
        |html: &str, selector: &str| -> Result<Array, Box<EvalAltResult>> {
            let document = Html::parse_document(html);
            let selector = Selector::parse(selector)
                .map_err(|e| script_err(format!("invalid selector: {e:?}")))?;
            Ok(document
                .select(&selector)
                .map(|element| Dynamic::from(element.text().collect::<String>()))
                .collect())
        },
    );
    module.set_native_fn(
        "select_attr",
        |html: &str, selector: &str, attr: &str| -> Result<Array, Box<EvalAltResult>> {
            let document = Html::parse_document(html);
            let selector = Selector::parse(selector)
                .map_err(|e| script_err(format!("invalid selector: {e:?}")))?;
            Ok(document
                .select(&selector)
                .filter_map(|element| element.value().attr(attr))
                .map(|value| Dynamic::from(value.to_string()))
                .collect())
        },
    );
    module
}

fn xlsx_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("sheets", |data: Blob| -> Result<Array, Box<EvalAltResult>> {
        let workbook = Xlsx::new(Cursor::new(data))
            .map_err(|e| script_err(format!("invalid spreadsheet: {e}")))?;
        Ok(workbook
            .sheet_names()
            .iter()
            .map(|name| Dynamic::from(name.clone()))
            .collect())
    });
    module.set_native_fn(
        "rows",
        |data: Blob, sheet: &str| -> Result<Array, Box<EvalAltResult>> {
            let mut workbook = Xlsx::new(Cursor::new(data))
                .map_err(|e| script_err(format!("invalid spreadsheet: {e}")))?;
            let range = workbook
                .worksheet_range(sheet)
                .map_err(|e| script_err(format!("no such sheet {sheet:?}: {e}")))?;
            let mut rows = Array::new();
            for row in range.rows() {
                let cells: Array = row
                    .iter()
                    .map(|cell| Dynamic::from(cell.to_string()))
                    .collect();
                rows.push(Dynamic::from(cells));
            }
            Ok(rows)
        },
    );
    module
}

fn zip_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("entries", |data: Blob| -> Result<Array, Box<EvalAltResult>> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))
            .map_err(|e| script_err(format!("invalid zip archive: {e}")))?;
        let mut names = Array::new();
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .map_err(|e| script_err(format!("corrupt zip entry: {e}")))?;
            names.push(Dynamic::from(entry.name().to_string()));
        }
        Ok(names)
    });
    module.set_native_fn(
        "read",
        |data: Blob, name: &str| -> Result<Blob, Box<EvalAltResult>> {
            let mut archive = zip::ZipArchive::new(Cursor::new(data))
                .map_err(|e| script_err(format!("invalid zip archive: {e}")))?;
            let mut entry = archive
                .by_name(name)
                .map_err(|e| script_err(format!("no such zip entry {name:?}: {e}")))?;
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| script_err(format!("could not read zip entry {name:?}: {e}")))?;
            Ok(contents)
        },
    );
    module
}

fn geo_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn(
        "distance",
        |lon1: f64, lat1: f64, lon2: f64, lat2: f64| -> Result<f64, Box<EvalAltResult>> {
            Ok(Point::new(lon1, lat1).haversine_distance(&Point::new(lon2, lat2)))
        },
    );
    module.set_native_fn(
        "bearing",
        |lon1: f64, lat1: f64, lon2: f64, lat2: f64| -> Result<f64, Box<EvalAltResult>> {
            Ok(Point::new(lon1, lat1).haversine_bearing(Point::new(lon2, lat2)))
        },
    );
    module
}
