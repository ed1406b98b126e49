use indoc::formatdoc;

use crate::DistBuildRequest;
use crate::config_settings::ConfigSettings;

/// Filename of the generated entry point, created inside the working
/// directory.
pub(crate) const BACKEND_SHIM_FILENAME: &str = "backend_shim.py";

/// Render the script that imports the build backend and drives its
/// `build_wheel` / `build_sdist` hooks.
///
/// The shim is the subprocess's sole entry point and reports produced
/// artifacts as `wheel: <filename>` / `sdist: <filename>` stdout lines;
/// anything else the backend prints is chatter. One shim covers both hooks so
/// a single merged input serves both kinds.
pub(crate) fn render_backend_shim(request: &DistBuildRequest, dist_dir: &str) -> String {
    // `module:object` per PEP 517; a bare module is itself the backend. The
    // object part may be a dotted attribute path, so resolve it by attribute
    // access rather than a `from` import.
    let (module, backend) = match request.build_system.build_backend.split_once(':') {
        Some((module, object)) => (module.to_string(), format!("{module}.{object}")),
        None => {
            let module = request.build_system.build_backend.clone();
            (module.clone(), module)
        }
    };
    formatdoc! {r#"
        # Autogenerated by the build frontend. DO NOT EDIT.
        import os

        import {module}

        backend = {backend}

        dist_dir = "{dist_dir}"
        os.makedirs(dist_dir, exist_ok=True)

        wheel_path = backend.build_wheel(dist_dir, {wheel_config_settings}) if {build_wheel} else None
        sdist_path = backend.build_sdist(dist_dir, {sdist_config_settings}) if {build_sdist} else None

        if wheel_path:
            print("wheel: {{}}".format(wheel_path))
        if sdist_path:
            print("sdist: {{}}".format(sdist_path))
    "#,
        dist_dir = escape_for_python(dist_dir),
        build_wheel = if request.build_wheel { "True" } else { "False" },
        build_sdist = if request.build_sdist { "True" } else { "False" },
        wheel_config_settings = config_settings_literal(request.wheel_config_settings.as_ref()),
        sdist_config_settings = config_settings_literal(request.sdist_config_settings.as_ref()),
    }
}

fn config_settings_literal(settings: Option<&ConfigSettings>) -> String {
    settings.map_or("None".to_string(), ConfigSettings::as_python_literal)
}

/// Keep an embedded path a valid Python string literal.
fn escape_for_python(path: &str) -> String {
    path.replace('\\', "\\\\").replace('"', "\\\"")
}
