mod common;

use std::fs;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use common::{CannedResponse, FakeServer, create_png_bytes, jpeg_like_bytes, unreachable_base_url, webp_like_bytes};
use tempfile::TempDir;
use transform_client::transform::{
    FsDownloadSink, HttpGateway, MemoryUrlPlatform, ObjectUrlPlatform, OperationKind, ParameterEdit, TransformConfig,
    TransformController, parse_edits, run_once,
};

struct Setup {
    controller: TransformController<HttpGateway>,
    platform: Arc<MemoryUrlPlatform>,
    downloads: TempDir,
    inputs: TempDir,
}

fn setup(base_url: &str) -> Setup {
    setup_with(base_url, |_| {})
}

fn setup_with(base_url: &str, adjust: impl FnOnce(&mut TransformConfig)) -> Setup {
    let mut config = TransformConfig::default();
    config.base_url = base_url.to_string();
    config.request_timeout_secs = 10;
    config.connect_timeout_secs = 2;
    config.download_grace_ms = 10;
    adjust(&mut config);

    let downloads = TempDir::new().expect("create download dir");
    let platform = Arc::new(MemoryUrlPlatform::new());
    let gateway = HttpGateway::new(&config).expect("gateway init");
    let controller = TransformController::new(
        config,
        gateway,
        platform.clone(),
        Arc::new(FsDownloadSink::new(downloads.path())),
    );

    Setup {
        controller,
        platform,
        downloads,
        inputs: TempDir::new().expect("create input dir"),
    }
}

fn write_input(setup: &Setup, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = setup.inputs.path().join(name);
    fs::write(&path, bytes).expect("write input file");
    path
}

#[tokio::test]
async fn compress_returns_preview_plus_download_with_ratio() {
    let compressed = jpeg_like_bytes(123_456);
    let envelope = format!(
        r#"{{"success":true,"original_size":500000,"compressed_size":123456,"preview":"{}","download_url":"data:image/jpeg;base64,{}"}}"#,
        general_purpose::STANDARD.encode(create_png_bytes(4, 4)),
        general_purpose::STANDARD.encode(&compressed)
    );
    let server = FakeServer::start(vec![CannedResponse::ok("application/json", envelope)]);
    let setup = setup(&server.base_url);
    let input = write_input(&setup, "big.jpg", &jpeg_like_bytes(500_000));

    let edits = parse_edits(OperationKind::Compress, &["quality=30", "lossless=false"]).expect("edits");
    let report = run_once(&setup.controller, OperationKind::Compress, &input, &edits)
        .await
        .expect("compress succeeds");

    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path(), "/compress");
    assert_eq!(requests[0].form_field("quality").as_deref(), Some("30"));
    assert_eq!(requests[0].form_field("lossless").as_deref(), Some("false"));
    assert_eq!(requests[0].form_field("subsampling").as_deref(), Some("1"));
    assert!(requests[0].has_file_part("big.jpg"));

    assert_eq!(report.result_kind, Some("previewPlusDownload"));
    let stats = report.stats.expect("stats present");
    assert!(stats.result_size < stats.original_size);
    assert_eq!(stats.reduction_ratio, 24.7);

    assert_eq!(report.download.file_name, "compressed.jpeg");
    assert_eq!(fs::read(&report.download.path).expect("read download"), compressed);
    assert!(report.download.path.starts_with(setup.downloads.path()));
}

#[tokio::test]
async fn convert_to_webp_names_result_with_webp_extension() {
    let server = FakeServer::start(vec![CannedResponse::ok("image/webp", webp_like_bytes())]);
    let setup = setup(&server.base_url);
    let input = write_input(&setup, "photo.png", &create_png_bytes(20, 20));

    let edits = parse_edits(OperationKind::Convert, &["format=webp"]).expect("edits");
    let report = run_once(&setup.controller, OperationKind::Convert, &input, &edits)
        .await
        .expect("convert succeeds");

    let requests = server.finish();
    assert_eq!(requests[0].path(), "/convert");
    assert_eq!(requests[0].form_field("format").as_deref(), Some("webp"));

    assert_eq!(report.result_kind, Some("blob"));
    assert_eq!(report.download.file_name, "photo.webp");
    assert_eq!(report.download.mime, "image/webp");
}

#[tokio::test]
async fn crop_outside_source_is_rejected_before_any_request() {
    // 没有服务监听：一旦发出请求就会得到 E_UNREACHABLE 而不是校验错误。
    let setup = setup(&unreachable_base_url());
    let input = write_input(&setup, "small.png", &create_png_bytes(50, 50));

    let edits = parse_edits(OperationKind::Crop, &["rect=10,10,100,100"]).expect("edits");
    let err = run_once(&setup.controller, OperationKind::Crop, &input, &edits)
        .await
        .expect_err("crop must be rejected");

    assert_eq!(err.code, "E_VALIDATION");
    assert_eq!(err.stage, "validate");
    assert_eq!(setup.controller.view().expect("view").status, "PreviewReady");
}

#[tokio::test]
async fn remote_json_error_is_surfaced_verbatim() {
    let server = FakeServer::start(vec![CannedResponse::with_status(
        400,
        "application/json",
        r#"{"error":"Invalid dimensions"}"#,
    )]);
    let setup = setup(&server.base_url);
    let input = write_input(&setup, "photo.png", &create_png_bytes(20, 20));

    let edits = parse_edits(OperationKind::Resize, &["width=0", "height=10"]).expect("edits");
    let err = run_once(&setup.controller, OperationKind::Resize, &input, &edits)
        .await
        .expect_err("validation rejects zero width");
    assert_eq!(err.code, "E_VALIDATION");

    setup
        .controller
        .edit(ParameterEdit::SetWidth(640))
        .await
        .expect("fix width");
    let view = setup.controller.submit().await.expect("submit");
    server.finish();

    assert_eq!(view.status, "Failed");
    assert_eq!(view.error_code, Some("E_REMOTE"));
    assert_eq!(view.error_message.as_deref(), Some("Invalid dimensions"));
}

#[tokio::test]
async fn unreachable_service_reports_network_error() {
    let setup = setup(&unreachable_base_url());
    let input = write_input(&setup, "photo.png", &create_png_bytes(20, 20));

    let err = run_once(&setup.controller, OperationKind::Convert, &input, &[])
        .await
        .expect_err("no server listening");

    assert_eq!(err.code, "E_UNREACHABLE");
    assert_eq!(err.stage, "network");
}

#[tokio::test]
async fn malformed_compress_body_is_decode_error() {
    let server = FakeServer::start(vec![CannedResponse::ok("application/json", "<html>not json</html>")]);
    let setup = setup(&server.base_url);
    let input = write_input(&setup, "photo.png", &create_png_bytes(20, 20));

    let err = run_once(&setup.controller, OperationKind::Compress, &input, &[])
        .await
        .expect_err("body is not the compress envelope");
    server.finish();

    assert_eq!(err.code, "E_MALFORMED_RESPONSE");
    assert_eq!(err.stage, "decode");
}

#[tokio::test]
async fn rotate_previews_then_downloads_with_server_filename() {
    let preview_jpeg = jpeg_like_bytes(256);
    let rotated = create_png_bytes(30, 20);
    let server = FakeServer::start(vec![
        CannedResponse::ok("image/jpeg", preview_jpeg.clone()),
        CannedResponse::ok("image/png", rotated.clone())
            .header("Content-Disposition", "attachment; filename=rotated_90_photo.png"),
    ]);
    let setup = setup(&server.base_url);
    let input = write_input(&setup, "photo.png", &create_png_bytes(20, 30));

    setup
        .controller
        .open_file(OperationKind::Rotate, &input)
        .await
        .expect("open");
    let view = setup
        .controller
        .edit(ParameterEdit::RotateBy(90))
        .await
        .expect("rotate");

    assert_eq!(view.angle, Some(90));
    let shown = view
        .preview_url
        .and_then(|url| setup.platform.resolve(&url))
        .expect("preview shown");
    assert_eq!(&shown[..], &preview_jpeg[..]);

    let emitted = setup.controller.download().await.expect("download");
    let requests = server.finish();

    assert_eq!(requests[0].path(), "/preview");
    assert_eq!(requests[0].form_field("angle").as_deref(), Some("90"));
    assert_eq!(requests[1].path(), "/rotate");
    assert_eq!(emitted.file_name, "rotated_90_photo.png");
    assert_eq!(fs::read(&emitted.path).expect("read download"), rotated);
    assert_eq!(setup.controller.view().expect("view").status, "Idle");
}

#[tokio::test]
async fn compress_download_url_is_fetched_from_server() {
    let server = FakeServer::start(vec![CannedResponse::ok("image/webp", webp_like_bytes())]);
    let download_url = server.url("files/out.webp");
    let envelope_server = FakeServer::start(vec![CannedResponse::ok(
        "application/json",
        format!(
            r#"{{"original_size":1000,"compressed_size":64,"preview":"{}","download_url":"{}"}}"#,
            general_purpose::STANDARD.encode(create_png_bytes(2, 2)),
            download_url
        ),
    )]);
    let setup = setup(&envelope_server.base_url);
    let input = write_input(&setup, "photo.png", &create_png_bytes(20, 20));

    let report = run_once(&setup.controller, OperationKind::Compress, &input, &[])
        .await
        .expect("compress succeeds");

    envelope_server.finish();
    let fetched = server.finish();

    assert_eq!(fetched[0].path(), "/files/out.webp");
    assert_eq!(report.download.file_name, "compressed.webp");
    assert_eq!(fs::read(&report.download.path).expect("read download"), webp_like_bytes());
}

#[tokio::test]
async fn handles_are_balanced_after_full_flow() {
    let server = FakeServer::start(vec![CannedResponse::ok("image/png", create_png_bytes(8, 8))]);
    let setup = setup(&server.base_url);
    let input = write_input(&setup, "photo.png", &create_png_bytes(20, 20));

    let edits = parse_edits(OperationKind::Resize, &["preset=instagram_post"]).expect("edits");
    let report = run_once(&setup.controller, OperationKind::Resize, &input, &edits)
        .await
        .expect("resize succeeds");
    let requests = server.finish();

    assert_eq!(requests[0].form_field("preset").as_deref(), Some("instagram_post"));
    assert_eq!(report.download.file_name, "resized-image.png");

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let stats = setup.controller.handle_stats().expect("stats");
    assert!(stats.is_balanced(), "unbalanced: {:?}", stats);
    assert_eq!(setup.platform.live_count(), 0);
}

#[tokio::test]
async fn oversized_result_body_is_resource_limit() {
    let server = FakeServer::start(vec![
        CannedResponse::ok("image/jpeg", jpeg_like_bytes(64 * 1024)),
        CannedResponse::ok("image/jpeg", jpeg_like_bytes(64 * 1024)).without_length(),
    ]);
    let setup = setup_with(&server.base_url, |config| config.max_file_size = 4096);
    let input = write_input(&setup, "photo.png", &create_png_bytes(8, 8));

    let declared = run_once(&setup.controller, OperationKind::Convert, &input, &[])
        .await
        .expect_err("declared length over limit");
    assert_eq!(declared.code, "E_RESOURCE_LIMIT");

    let streamed = run_once(&setup.controller, OperationKind::Convert, &input, &[])
        .await
        .expect_err("streamed body over limit");
    server.finish();

    assert_eq!(streamed.code, "E_RESOURCE_LIMIT");
    assert_eq!(streamed.stage, "local");
    assert!(fs::read_dir(setup.downloads.path()).expect("list downloads").next().is_none());
}

#[tokio::test]
async fn oversized_error_body_is_cut_to_generic_message() {
    let mut body = br#"{"error":""#.to_vec();
    body.resize(16 * 1024, b'x');
    body.extend_from_slice(br#""}"#);
    let server = FakeServer::start(vec![CannedResponse::with_status(500, "application/json", body)]);
    let setup = setup_with(&server.base_url, |config| config.max_error_body_bytes = 1024);
    let input = write_input(&setup, "photo.png", &create_png_bytes(8, 8));

    setup
        .controller
        .open_file(OperationKind::Convert, &input)
        .await
        .expect("open");
    let view = setup.controller.submit().await.expect("submit");
    server.finish();

    assert_eq!(view.status, "Failed");
    assert_eq!(view.error_code, Some("E_REMOTE"));
    assert_eq!(view.error_message.as_deref(), Some("图片处理失败（HTTP 500）"));
}
