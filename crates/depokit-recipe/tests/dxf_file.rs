use depokit_core::{Command, LengthUnit, Point};
use depokit_recipe::{
    import_file, prepare_recipe, BuildOptions, DxfImportError, DxfImportOptions, RecipeError,
};
use dxf::entities::{Entity, EntityType, Line, LwPolyline};
use dxf::LwPolylineVertex;
use dxf::enums::AcadVersion;
use dxf::Drawing;

fn new_drawing() -> Drawing {
    let mut drawing = Drawing::new();
    drawing.header.version = AcadVersion::R2000;
    drawing
}

fn square_drawing() -> Drawing {
    let mut drawing = new_drawing();
    let mut square = LwPolyline::default();
    for (x, y) in [(10.0, 10.0), (20.0, 10.0), (20.0, 20.0), (10.0, 20.0)] {
        square.vertices.push(LwPolylineVertex {
            x,
            y,
            ..Default::default()
        });
    }
    square.flags = 1;
    drawing.add_entity(Entity::new(EntityType::LwPolyline(square)));
    drawing.add_entity(Entity::new(EntityType::Line(Line::new(
        dxf::Point::new(25.0, 10.0, 0.0),
        dxf::Point::new(25.0, 20.0, 0.0),
    ))));
    drawing
}

#[test]
fn test_file_import_and_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("square.dxf");
    square_drawing().save_file(&path).unwrap();

    let (geometry, output) = prepare_recipe(
        &path,
        &DxfImportOptions::default(),
        BuildOptions::default(),
    )
    .unwrap();

    assert_eq!(geometry.unit, LengthUnit::Millimeter);
    assert_eq!(geometry.path_count, 2);
    assert!(geometry.paths[0].closed);

    let recipe = &output.recipe;
    assert_eq!(recipe.metadata().source.as_deref(), Some("square.dxf"));
    assert_eq!(recipe.first_position(), Some(Point::new(0.0, 0.0)));
    // travel, three edges and the closing edge, then travel and one print
    assert_eq!(recipe.len(), 7);
    assert_eq!(recipe.get(5).and_then(Command::target), Some(Point::new(15.0, 0.0)));
    let bbox = recipe.metadata().bounding_box.unwrap();
    assert_eq!((bbox.max_x, bbox.max_y), (15.0, 10.0));
}

#[test]
fn test_missing_file_is_reported() {
    let err = import_file("/nonexistent/drawing.dxf", &DxfImportOptions::default()).unwrap_err();
    assert!(matches!(err, DxfImportError::Io { .. }));
    assert!(err.to_string().contains("drawing.dxf"));
}

#[test]
fn test_geometry_outside_workspace_fails_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("large.dxf");
    let mut drawing = new_drawing();
    drawing.add_entity(Entity::new(EntityType::Line(Line::new(
        dxf::Point::new(0.0, 0.0, 0.0),
        dxf::Point::new(80.0, 0.0, 0.0),
    ))));
    drawing.save_file(&path).unwrap();

    let err = prepare_recipe(&path, &DxfImportOptions::default(), BuildOptions::default())
        .unwrap_err();
    assert!(matches!(err, RecipeError::Validation(_)));
    assert!(err.is_validation());
}
