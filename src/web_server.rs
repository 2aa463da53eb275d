use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, App, HttpResponse, HttpServer};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::{self, AuthUser};
use crate::config::AppConfig;
use crate::db::{ImageRecord, NewImage, Store};
use crate::error::AppError;
use crate::exif::read_exif_map;
use crate::normalize::{lat_lon, normalize, to_rows};

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct MeResponse {
    id: i64,
    email: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    image: ImageRecord,
    metadata: serde_json::Value,
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AppError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email address is required".into()));
    }
    if password.len() < 8 {
        return Err(AppError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

async fn register(
    store: web::Data<Store>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, AppError> {
    validate_credentials(&payload.email, &payload.password)?;
    let hash = auth::hash_password(&payload.password)?;
    let user = store.create_user(&payload.email, &hash).await?;
    Ok(HttpResponse::Created().json(MeResponse {
        id: user.id,
        email: user.email,
    }))
}

async fn login(
    config: web::Data<AppConfig>,
    store: web::Data<Store>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let user = store
        .user_by_email(&payload.email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !auth::verify_password(&payload.password, &user.password_hash)? {
        log::warn!("Failed authentication attempt for '{}'", user.email);
        return Err(AppError::InvalidCredentials);
    }

    let token = auth::sign(
        user.id,
        &user.email,
        &config.jwt_secret,
        config.token_lifetime_hours,
    )?;
    log::info!("User '{}' authenticated", user.email);
    Ok(HttpResponse::Ok().json(LoginResponse {
        token,
        email: user.email,
    }))
}

async fn me(auth: AuthUser, store: web::Data<Store>) -> Result<HttpResponse, AppError> {
    let user = store
        .user_by_id(auth.user_id)
        .await?
        .ok_or(AppError::TokenInvalid)?;
    Ok(HttpResponse::Ok().json(MeResponse {
        id: user.id,
        email: user.email,
    }))
}

/// What the blocking pipeline learned about a stored upload.
struct Analysis {
    rows: Vec<(String, String)>,
    coords: Option<(f64, f64)>,
    file_hash: Option<String>,
    dimensions: Option<(u32, u32)>,
}

/// Extract, normalize, hash, and probe dimensions. Runs on the blocking pool;
/// every failure inside degrades to "no data" rather than failing the upload.
fn analyze_upload(path: &Path) -> Analysis {
    let metadata = normalize(read_exif_map(path));
    let coords = lat_lon(&metadata);
    let rows = to_rows(&metadata);

    let file_hash = match file_sha256(path) {
        Ok(hash) => Some(hash),
        Err(e) => {
            log::warn!("Could not hash {:?}: {}", path, e);
            None
        }
    };

    let dimensions = match image::image_dimensions(path) {
        Ok(dims) => Some(dims),
        Err(e) => {
            log::warn!("Could not get dimensions for {:?}: {}", path, e);
            None
        }
    };

    Analysis {
        rows,
        coords,
        file_hash,
        dimensions,
    }
}

fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn allowed_extension(filename: &str, allowed: &HashSet<String>) -> Result<String, AppError> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| allowed.contains(ext))
        .ok_or_else(|| AppError::InvalidFileType(filename.to_string()))
}

/// Receive the multipart `file` field, store it under a fresh UUID name, and
/// run the decode-extract-normalize-persist pipeline.
async fn upload_image(
    auth: AuthUser,
    config: web::Data<AppConfig>,
    store: web::Data<Store>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    log::debug!("Upload started by '{}'", auth.email);
    let mut saved: Option<(String, PathBuf, String)> = None;

    while let Some(mut field) = payload.try_next().await? {
        if field.name() != "file" {
            while field.try_next().await?.is_some() {}
            continue;
        }

        let original = field
            .content_disposition()
            .get_filename()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest("Upload has no filename".into()))?;
        let extension = allowed_extension(&original, &config.allowed_extensions)?;

        let unique_filename = format!("{}.{}", Uuid::new_v4(), extension);
        let path = Path::new(&config.upload_directory).join(&unique_filename);
        log::debug!("Storing upload '{}' as {:?}", original, path);

        let create_path = path.clone();
        let mut file = web::block(move || std::fs::File::create(&create_path)).await??;
        let mut written = 0usize;
        while let Some(chunk) = field.try_next().await? {
            written += chunk.len();
            if written > config.max_upload_bytes {
                drop(file);
                let stale = path.clone();
                let _ = web::block(move || std::fs::remove_file(&stale)).await;
                log::warn!("Rejected oversize upload '{}' ({} bytes in)", original, written);
                return Err(AppError::PayloadTooLarge);
            }
            file = web::block(move || file.write_all(&chunk).map(|_| file)).await??;
        }

        saved = Some((unique_filename, path, extension));
        break;
    }

    let (unique_filename, path, extension) =
        saved.ok_or_else(|| AppError::BadRequest("No file part in upload".into()))?;

    let analyze_path = path.clone();
    let analysis = web::block(move || analyze_upload(&analyze_path)).await?;

    let new = NewImage {
        user_id: auth.user_id,
        filename: unique_filename,
        file_path: path.to_string_lossy().to_string(),
        file_extension: extension,
        file_hash: analysis.file_hash,
        width: analysis.dimensions.map(|(w, _)| w as i64),
        height: analysis.dimensions.map(|(_, h)| h as i64),
        latitude: analysis.coords.map(|(lat, _)| lat),
        longitude: analysis.coords.map(|(_, lon)| lon),
    };
    let image = store.create_image(new, &analysis.rows).await?;

    Ok(HttpResponse::Created().json(UploadResponse {
        image,
        metadata: rows_to_json(&analysis.rows),
    }))
}

async fn list_images(auth: AuthUser, store: web::Data<Store>) -> Result<HttpResponse, AppError> {
    let images = store.images_for_user(auth.user_id).await?;
    Ok(HttpResponse::Ok().json(images))
}

/// Fetch an image row, 404 if absent, 403 unless the caller owns it.
async fn owned_image(store: &Store, id: i64, user_id: i64) -> Result<ImageRecord, AppError> {
    let image = store
        .image_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("image {}", id)))?;
    if image.user_id != user_id {
        log::warn!("User {} denied access to image {}", user_id, id);
        return Err(AppError::Forbidden);
    }
    Ok(image)
}

fn rows_to_json(rows: &[(String, String)]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = rows
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(map)
}

async fn get_metadata(
    auth: AuthUser,
    store: web::Data<Store>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let image = owned_image(&store, path.into_inner(), auth.user_id).await?;
    let rows = store.metadata_for_image(image.id).await?;
    Ok(HttpResponse::Ok().json(rows_to_json(&rows)))
}

async fn download_metadata(
    auth: AuthUser,
    store: web::Data<Store>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let image = owned_image(&store, path.into_inner(), auth.user_id).await?;
    let rows = store.metadata_for_image(image.id).await?;
    Ok(HttpResponse::Ok()
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=metadata_{}.json", image.id),
        ))
        .json(rows_to_json(&rows)))
}

async fn clear_metadata(
    auth: AuthUser,
    store: web::Data<Store>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let image = owned_image(&store, path.into_inner(), auth.user_id).await?;
    let cleared = store.clear_metadata(image.id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cleared": cleared })))
}

async fn delete_image(
    auth: AuthUser,
    store: web::Data<Store>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let image = owned_image(&store, path.into_inner(), auth.user_id).await?;
    store.delete_image(image.id).await?;

    let stored = PathBuf::from(&image.file_path);
    if let Err(e) = web::block(move || std::fs::remove_file(&stored)).await? {
        log::warn!("Could not remove stored file for image {}: {}", image.id, e);
    }
    Ok(HttpResponse::NoContent().finish())
}

async fn serve_image(
    _auth: AuthUser,
    config: web::Data<AppConfig>,
    path: web::Path<String>,
) -> Result<NamedFile, AppError> {
    let filename = path.into_inner();
    if filename.contains('/') || filename.contains("..") {
        return Err(AppError::BadRequest("Invalid filename".into()));
    }
    let file_path = Path::new(&config.upload_directory).join(&filename);
    log::trace!("Serving upload from: {:?}", file_path);
    NamedFile::open_async(&file_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(format!("upload {}", filename))
        } else {
            AppError::Io(e)
        }
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/me", web::get().to(me)),
    )
    .route("/upload", web::post().to(upload_image))
    .route("/images", web::get().to(list_images))
    .route("/images/{id}", web::delete().to(delete_image))
    .service(
        web::resource("/images/{id}/metadata")
            .route(web::get().to(get_metadata))
            .route(web::delete().to(clear_metadata)),
    )
    .route(
        "/images/{id}/metadata/download",
        web::get().to(download_metadata),
    )
    .route("/uploads/{filename}", web::get().to(serve_image));
}

pub async fn start_web_server(config: AppConfig, store: Store) -> std::io::Result<()> {
    let port = config.web_port;
    let config_data = web::Data::new(config);
    let store_data = web::Data::new(store);

    log::info!("Starting web server on port: {}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(store_data.clone())
            .configure(configure)
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}
