use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use rhai::{Array, Dynamic, EvalAltResult, Module};

use crate::env::TransformEnv;
use crate::script::script_err;
use crate::utils::{files_with_extensions, yamls_with_kind};

/// Builds the `fs` module exposed to scripts. Every function validates its
/// path arguments against the transformer's allow-set before touching the
/// filesystem.
pub fn fs_module(env: Rc<TransformEnv>) -> Module {
    let mut module = Module::new();

    let guard = env.clone();
    module.set_native_fn("exists", move |path: &str| -> Result<bool, Box<EvalAltResult>> {
        let path = checked(&guard, path)?;
        Ok(path.exists())
    });

    let guard = env.clone();
    module.set_native_fn("read", move |path: &str| -> Result<Dynamic, Box<EvalAltResult>> {
        let path = checked(&guard, path)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Dynamic::from(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Dynamic::UNIT),
            Err(err) => Err(script_err(format!(
                "could not read file {}: {err}",
                path.display()
            ))),
        }
    });

    let guard = env.clone();
    module.set_native_fn(
        "read_dir",
        move |path: &str| -> Result<Array, Box<EvalAltResult>> {
            let path = checked(&guard, path)?;
            let entries = std::fs::read_dir(&path).map_err(|err| {
                script_err(format!("could not read directory {}: {err}", path.display()))
            })?;
            let mut names = Array::new();
            for entry in entries {
                let entry = entry.map_err(|err| script_err(err.to_string()))?;
                names.push(Dynamic::from(
                    entry.file_name().to_string_lossy().into_owned(),
                ));
            }
            names.sort_by_key(|d| d.clone().into_string().unwrap_or_default());
            Ok(names)
        },
    );

    let guard = env.clone();
    module.set_native_fn("is_dir", move |path: &str| -> Result<bool, Box<EvalAltResult>> {
        let path = checked(&guard, path)?;
        let metadata = std::fs::metadata(&path)
            .map_err(|_| script_err("unable to retrieve file information"))?;
        Ok(metadata.is_dir())
    });

    let guard = env.clone();
    module.set_native_fn(
        "write",
        move |path: &str, data: &str| -> Result<i64, Box<EvalAltResult>> {
            write_impl(&guard, path, data, None)
        },
    );
    let guard = env.clone();
    module.set_native_fn(
        "write",
        move |path: &str, data: &str, perm: i64| -> Result<i64, Box<EvalAltResult>> {
            write_impl(&guard, path, data, Some(perm))
        },
    );

    let guard = env.clone();
    module.set_native_fn(
        "path_join",
        move |a: &str, b: &str| -> Result<String, Box<EvalAltResult>> {
            let joined = Path::new(a).join(b);
            let joined = checked(&guard, &joined.to_string_lossy())?;
            Ok(joined.to_string_lossy().into_owned())
        },
    );

    let guard = env.clone();
    module.set_native_fn(
        "path_base",
        move |path: &str| -> Result<String, Box<EvalAltResult>> {
            let path = checked(&guard, path)?;
            Ok(path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default())
        },
    );

    let guard = env.clone();
    module.set_native_fn(
        "path_rel",
        move |base: &str, target: &str| -> Result<String, Box<EvalAltResult>> {
            let base = checked(&guard, base)?;
            let target = checked(&guard, target)?;
            relative_path(&base, &target)
                .map(|p| p.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    script_err(format!(
                        "cannot make {} relative to {}",
                        target.display(),
                        base.display()
                    ))
                })
        },
    );

    let guard = env.clone();
    module.set_native_fn(
        "get_files_with_pattern",
        move |path: &str, ext: &str| -> Result<Array, Box<EvalAltResult>> {
            let path = checked(&guard, path)?;
            let ext = ext.trim_start_matches('.');
            let files = files_with_extensions(&path, &[ext])
                .map_err(|e| script_err(e.to_string()))?;
            Ok(paths_to_array(files))
        },
    );

    let guard = env.clone();
    module.set_native_fn(
        "get_yamls_with_type_meta",
        move |path: &str, kind: &str| -> Result<Array, Box<EvalAltResult>> {
            if kind.is_empty() {
                return Err(script_err("kind is missing in find parameters"));
            }
            let path = checked(&guard, path)?;
            let files = yamls_with_kind(&path, kind).map_err(|e| script_err(e.to_string()))?;
            Ok(paths_to_array(files))
        },
    );

    let guard = env.clone();
    module.set_native_fn(
        "find_xml_path",
        move |file: &str, xpath: &str| -> Result<Array, Box<EvalAltResult>> {
            if xpath.is_empty() {
                return Err(script_err("xml path expression is missing in find parameters"));
            }
            let path = checked(&guard, file)?;
            let text = std::fs::read_to_string(&path).map_err(|_| {
                script_err(format!("could not read file in path: {}", path.display()))
            })?;
            find_xml_path(&text, xpath)
        },
    );

    module
}

/// Evaluates an xpath expression against an XML document, stringifying
/// every kind of result the way scripts expect: scalars become a
/// single-element list, node sets one entry per node in document order.
fn find_xml_path(text: &str, xpath: &str) -> Result<Array, Box<EvalAltResult>> {
    let package = sxd_document::parser::parse(text)
        .map_err(|e| script_err(format!("could not parse xml file: {e:?}")))?;
    let document = package.as_document();
    let value = sxd_xpath::evaluate_xpath(&document, xpath)
        .map_err(|e| script_err(format!("could not compile the xml path expression: {e:?}")))?;

    let mut result = Array::new();
    match value {
        sxd_xpath::Value::Boolean(b) => result.push(Dynamic::from(b.to_string())),
        sxd_xpath::Value::Number(n) => result.push(Dynamic::from(n.to_string())),
        sxd_xpath::Value::String(s) => result.push(Dynamic::from(s)),
        sxd_xpath::Value::Nodeset(nodes) => {
            for node in nodes.document_order() {
                result.push(Dynamic::from(node.string_value()));
            }
        }
    }
    Ok(result)
}

/// Validates a script-supplied path and returns it as a `PathBuf`.
fn checked(env: &TransformEnv, path: &str) -> Result<PathBuf, Box<EvalAltResult>> {
    let path = PathBuf::from(path);
    if !env.is_path_valid(&path) {
        return Err(script_err("invalid path"));
    }
    Ok(path)
}

fn write_impl(
    env: &TransformEnv,
    path: &str,
    data: &str,
    perm: Option<i64>,
) -> Result<i64, Box<EvalAltResult>> {
    if path.is_empty() {
        return Err(script_err("filepath is missing in write parameters"));
    }
    let path = checked(env, path)?;
    std::fs::write(&path, data)
        .map_err(|err| script_err(format!("could not write to file {}: {err}", path.display())))?;
    if let Some(perm) = perm {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(perm as u32);
        std::fs::set_permissions(&path, permissions)
            .map_err(|err| script_err(format!("could not set permissions: {err}")))?;
    }
    Ok(data.len() as i64)
}

fn paths_to_array(paths: Vec<PathBuf>) -> Array {
    paths
        .into_iter()
        .map(|p| Dynamic::from(p.to_string_lossy().into_owned()))
        .collect()
}

/// Computes `target` relative to `base` for two absolute paths.
fn relative_path(base: &Path, target: &Path) -> Option<PathBuf> {
    let base_components: Vec<Component> = base.components().collect();
    let target_components: Vec<Component> = target.components().collect();

    let common = base_components
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    Some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_xml_path_returns_node_values_in_document_order() {
        let xml = "<project><modules><module>core</module><module>cli</module></modules></project>";
        let values = find_xml_path(xml, "/project/modules/module").unwrap();
        let values: Vec<String> = values
            .into_iter()
            .map(|v| v.into_string().unwrap())
            .collect();
        assert_eq!(values, vec!["core", "cli"]);
    }

    #[test]
    fn find_xml_path_stringifies_scalar_results() {
        let xml = "<deps><dep/><dep/></deps>";
        let values = find_xml_path(xml, "count(/deps/dep)").unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].clone().into_string().unwrap(), "2");
    }

    #[test]
    fn relative_path_walks_up_and_down() {
        assert_eq!(
            relative_path(Path::new("/a/b"), Path::new("/a/c/d")),
            Some(PathBuf::from("../c/d"))
        );
        assert_eq!(
            relative_path(Path::new("/a"), Path::new("/a")),
            Some(PathBuf::from("."))
        );
    }
}
